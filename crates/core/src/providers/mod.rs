pub mod openai;

pub use openai::{HttpCompletionModel, HttpEmbedder, HttpProviderConfig};
