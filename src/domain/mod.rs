// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Pure Rust types and algorithms that define what the system
// works with, independent of the tensor framework:
//
//   sample.rs  — a pre-tokenised question/context example
//   span.rs    — answer spans, predictions and the O(n) span
//                decoder that turns start/end distributions into
//                one best contiguous span
//   options.rs — closed enums for every string tag accepted in
//                hyper-parameter files ("max", "conv", ...)
//   error.rs   — typed errors raised while validating config,
//                samples and checkpoints
//   traits.rs  — seams the application layer programs against
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - serde derives are fine (configs are persisted as JSON)

/// Typed configuration / checkpoint / sample errors
pub mod error;

/// String-tagged options resolved into closed enums
pub mod options;

/// A pre-tokenised reading-comprehension example
pub mod sample;

/// Answer spans and the span decoder
pub mod span;

/// Core abstractions (traits) that other layers implement
pub mod traits;
