pub mod sequential;
pub mod simple_cnn;

pub use sequential::Sequential;
pub use simple_cnn::{SimpleCnn, SimpleCnnConfig};
