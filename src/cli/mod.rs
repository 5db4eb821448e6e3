pub mod archive;
pub mod extract;
pub mod info;

pub use archive::*;
pub use extract::*;
pub use info::*;
