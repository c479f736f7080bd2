use tch::{nn, nn::RNN, Tensor};

use crate::config::ModelConfig;

/// Token embedding, LSTM and vocabulary projection. The image embedding is
/// fed as the first step of the sequence.
pub struct Decoder {
    embed: nn::Embedding,
    lstm: nn::LSTM,
    linear: nn::Linear,
    dropout: f64,
}

impl Decoder {
    pub fn new(vs: &nn::Path, config: &ModelConfig) -> Self {
        let embed = nn::embedding(vs / "embed", config.vocab_size, config.embed_size, Default::default());
        let lstm_config = nn::RNNConfig {
            num_layers: config.num_layers,
            batch_first: true,
            ..Default::default()
        };
        let lstm = nn::lstm(vs / "lstm", config.embed_size, config.hidden_size, lstm_config);
        let linear = nn::linear(vs / "linear", config.hidden_size, config.vocab_size, Default::default());

        Self {
            embed,
            lstm,
            linear,
            dropout: config.dropout,
        }
    }

    /// features: [batch, embed_size]
    /// captions: [batch, seq_len] token ids
    /// Returns: logits [batch, seq_len + 1, vocab_size]; position 0 is the
    /// image step, position t > 0 follows `captions[:, t - 1]`.
    pub fn forward_t(&self, features: &Tensor, captions: &Tensor, train: bool) -> Tensor {
        let embeddings = captions.apply(&self.embed).dropout(self.dropout, train);
        let inputs = Tensor::cat(&[features.unsqueeze(1), embeddings], 1);
        let (hiddens, _) = self.lstm.seq(&inputs);
        hiddens.apply(&self.linear)
    }
}
