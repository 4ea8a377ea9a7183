//! Typed lookups over an already parsed tag document.

use nbt::CompoundTag;

/// Read access to a compound node of a parsed tag tree.
///
/// Every lookup is optional: a missing key or a value of another type yields
/// `None`, and the `*_or` variants fall back to a default.
pub trait TagCompound {
    fn int(&self, name: &str) -> Option<i32>;

    fn byte(&self, name: &str) -> Option<i8>;

    fn text<'a>(&'a self, name: &'a str) -> Option<&'a str>;

    fn compound<'a>(&'a self, name: &'a str) -> Option<&'a Self>;

    fn compound_list<'a>(&'a self, name: &'a str) -> Option<Vec<&'a Self>>;

    fn long_array<'a>(&'a self, name: &'a str) -> Option<&'a [i64]>;

    fn contains(&self, name: &str) -> bool;

    fn int_or(&self, name: &str, default: i32) -> i32 {
        self.int(name).unwrap_or(default)
    }

    fn byte_or(&self, name: &str, default: i8) -> i8 {
        self.byte(name).unwrap_or(default)
    }

    fn text_or<'a>(&'a self, name: &'a str, default: &'a str) -> &'a str {
        self.text(name).unwrap_or(default)
    }
}

impl TagCompound for CompoundTag {
    fn int(&self, name: &str) -> Option<i32> {
        self.get_i32(name).ok()
    }

    fn byte(&self, name: &str) -> Option<i8> {
        self.get_i8(name).ok()
    }

    fn text<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        self.get_str(name).ok()
    }

    fn compound<'a>(&'a self, name: &'a str) -> Option<&'a Self> {
        self.get_compound_tag(name).ok()
    }

    fn compound_list<'a>(&'a self, name: &'a str) -> Option<Vec<&'a Self>> {
        self.get_compound_tag_vec(name).ok()
    }

    fn long_array<'a>(&'a self, name: &'a str) -> Option<&'a [i64]> {
        self.get_i64_vec(name).ok().map(|values| values.as_slice())
    }

    fn contains(&self, name: &str) -> bool {
        self.contains_key(name)
    }
}
