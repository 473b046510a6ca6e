pub mod observer;
pub mod obstruction;
pub mod resolution;

pub use self::{
    observer::*,
    obstruction::*,
    resolution::*,
};
