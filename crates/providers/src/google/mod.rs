pub mod config;
pub mod genai;
pub mod imagen;
pub mod vertex;
pub mod wire;
