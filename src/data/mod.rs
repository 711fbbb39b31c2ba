// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Tokenisation and vocabulary building happen upstream; this
// layer only moves already-mapped ids into tensors:
//
//   samples.jsonl
//       │
//       ▼
//   JsonlLoader   → parses one RcSample per line, drops broken
//                   ones and ids outside the vocabulary
//       │
//       ▼
//   split_train_val → seeded shuffle + split
//       │
//       ▼
//   RcDataset     → implements Burn's Dataset trait, yields
//                   seeded shuffled mini-batches of samples
//       │
//       ▼
//   RcBatcher     → pads a mini-batch and derives validity masks
//
// Pretrained word vectors enter through `load_embedding_table`,
// a side input to training.
//
// Reference: Burn Book §4 (Datasets)

/// Reads pre-tokenised samples from JSON lines
pub mod loader;

/// Implements Burn's Dataset trait for reading-comprehension samples
pub mod dataset;

/// Pads samples into tensors with validity masks
pub mod batcher;

/// Shuffles and splits data into train/validation sets
pub mod splitter;

/// Reads pretrained word vectors in vocabulary order
pub mod embeddings;
