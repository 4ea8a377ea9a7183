//! Packed 32-bit cell and shaft values.
//!
//! Every field is replaced with a mask-and-merge so writing one field never
//! disturbs the bits of another.

/// Contents field mask (bits 0-9).
const CONTENTS_MASK: u32 = 0x0000_03FF;
/// Light field mask (bits 10-13).
const LIGHT_MASK: u32 = 0x0000_3C00;
/// Data field mask (bits 14-31).
const DATA_MASK: u32 = 0xFFFF_C000;

/// Cell field within a packed cell value.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CellField {
    Contents,
    Light,
    Data,
}

impl CellField {
    pub const ALL: [CellField; 3] = [CellField::Contents, CellField::Light, CellField::Data];

    fn mask(self) -> u32 {
        match self {
            CellField::Contents => CONTENTS_MASK,
            CellField::Light => LIGHT_MASK,
            CellField::Data => DATA_MASK,
        }
    }

    fn shift(self) -> u32 {
        self.mask().trailing_zeros()
    }
}

/// Shaft (column) field within a packed shaft value.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ShaftField {
    TopHeight,
    Temperature,
    Humidity,
    BottomHeight,
    SunlightHeight,
}

impl ShaftField {
    pub const ALL: [ShaftField; 5] = [
        ShaftField::TopHeight,
        ShaftField::Temperature,
        ShaftField::Humidity,
        ShaftField::BottomHeight,
        ShaftField::SunlightHeight,
    ];

    fn mask(self) -> u32 {
        match self {
            ShaftField::TopHeight => 0x0000_00FF,
            ShaftField::Temperature => 0x0000_0F00,
            ShaftField::Humidity => 0x0000_F000,
            ShaftField::BottomHeight => 0x00FF_0000,
            ShaftField::SunlightHeight => 0xFF00_0000,
        }
    }

    fn shift(self) -> u32 {
        self.mask().trailing_zeros()
    }
}

fn extract(value: u32, mask: u32, shift: u32) -> u32 {
    (value & mask) >> shift
}

fn replace(value: u32, mask: u32, shift: u32, field: u32) -> u32 {
    value ^ ((value ^ (field << shift)) & mask)
}

/// Palette colors understood by paintable blocks.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Color {
    White = 0,
    PaleCyan,
    Pink,
    PaleBlue,
    Yellow,
    PaleGreen,
    Salmon,
    LightGray,
    Gray,
    Cyan,
    Purple,
    Blue,
    Brown,
    Green,
    Red,
    Black,
}

/// Single voxel value: contents, light and data.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct Cell(pub u32);

impl Cell {
    pub const AIR: Cell = Cell(0);

    pub fn new(contents: u32, light: u32, data: u32) -> Cell {
        Cell(0)
            .with_contents(contents)
            .with_light(light)
            .with_data(data)
    }

    pub fn from_contents(contents: u32) -> Cell {
        Cell(contents & CONTENTS_MASK)
    }

    pub fn field(self, field: CellField) -> u32 {
        extract(self.0, field.mask(), field.shift())
    }

    pub fn with_field(self, field: CellField, value: u32) -> Cell {
        Cell(replace(self.0, field.mask(), field.shift(), value))
    }

    pub fn contents(self) -> u32 {
        self.field(CellField::Contents)
    }

    pub fn light(self) -> u32 {
        self.field(CellField::Light)
    }

    pub fn data(self) -> u32 {
        self.field(CellField::Data)
    }

    pub fn with_contents(self, contents: u32) -> Cell {
        self.with_field(CellField::Contents, contents)
    }

    pub fn with_light(self, light: u32) -> Cell {
        self.with_field(CellField::Light, light)
    }

    pub fn with_data(self, data: u32) -> Cell {
        self.with_field(CellField::Data, data)
    }

    /// Sets the paint bit and color bits in the low five data bits.
    pub fn paint(self, color: Color) -> Cell {
        let data = (self.data() & !0x1F) | 1 | ((color as u32) << 1);
        self.with_data(data)
    }

    /// Paints a stair block, whose color lives in data bits 5-9.
    pub fn paint_stair(self, color: Color) -> Cell {
        let data = (self.data() & !0x3E0) | 0x20 | (((color as u32) & 0xF) << 6);
        self.with_data(data)
    }

    /// Marks the topmost cell of a fluid column.
    pub fn with_top_flag(self) -> Cell {
        self.with_data(self.data() | 0x10)
    }

    /// Replaces the low four data bits (fence connections).
    pub fn with_variant(self, variant: u32) -> Cell {
        self.with_data((self.data() & !0xF) | (variant & 0xF))
    }

    pub fn with_stair_rotation(self, rotation: u32) -> Cell {
        self.with_data((self.data() & !0x3) | (rotation & 0x3))
    }

    pub fn with_upside_down(self, upside_down: bool) -> Cell {
        if upside_down {
            self.with_data(self.data() | 0x4)
        } else {
            self.with_data(self.data() & !0x4)
        }
    }
}

/// Per-column metadata value.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct Shaft(pub u32);

impl Shaft {
    pub fn field(self, field: ShaftField) -> u32 {
        extract(self.0, field.mask(), field.shift())
    }

    pub fn with_field(self, field: ShaftField, value: u32) -> Shaft {
        Shaft(replace(self.0, field.mask(), field.shift(), value))
    }

    pub fn top_height(self) -> u32 {
        self.field(ShaftField::TopHeight)
    }

    pub fn temperature(self) -> u32 {
        self.field(ShaftField::Temperature)
    }

    pub fn humidity(self) -> u32 {
        self.field(ShaftField::Humidity)
    }

    pub fn bottom_height(self) -> u32 {
        self.field(ShaftField::BottomHeight)
    }

    pub fn sunlight_height(self) -> u32 {
        self.field(ShaftField::SunlightHeight)
    }

    pub fn with_top_height(self, value: u32) -> Shaft {
        self.with_field(ShaftField::TopHeight, value)
    }

    pub fn with_temperature(self, value: u32) -> Shaft {
        self.with_field(ShaftField::Temperature, value)
    }

    pub fn with_humidity(self, value: u32) -> Shaft {
        self.with_field(ShaftField::Humidity, value)
    }

    pub fn with_bottom_height(self, value: u32) -> Shaft {
        self.with_field(ShaftField::BottomHeight, value)
    }

    pub fn with_sunlight_height(self, value: u32) -> Shaft {
        self.with_field(ShaftField::SunlightHeight, value)
    }
}
