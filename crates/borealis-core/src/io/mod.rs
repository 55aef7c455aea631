pub mod fits;

pub use fits::{read_fits, read_header, write_fits, CardValue, FitsReader, Header};
