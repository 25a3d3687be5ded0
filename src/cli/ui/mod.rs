mod painter;
mod table;

pub(crate) use self::painter::Painter;
pub(crate) use self::table::Table;
