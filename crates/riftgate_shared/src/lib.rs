pub mod layers;
pub mod plane;
pub mod slice;
pub mod trigger;
