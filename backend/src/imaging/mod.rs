pub mod codec;
pub mod compositor;
