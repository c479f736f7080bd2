pub mod error;
pub mod vocab;
pub mod word;

pub use error::TokenizerError;
pub use vocab::{Vocabulary, EOS_TOKEN, PAD_TOKEN, SOS_TOKEN, UNK_TOKEN};
pub use word::{Tokenize, WordTokenizer};
