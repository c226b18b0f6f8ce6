pub mod enums;
pub mod intake;
pub mod medication;
pub mod owner;
pub mod slot;

pub use intake::*;
pub use medication::*;
pub use owner::*;
pub use slot::*;
