// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Persistence shared by training and inference:
//
//   checkpoint.rs — model records under debug/ and epoch/ with
//                   their retention policies, plus the
//                   hyper-parameter file that lets inference
//                   rebuild the architecture
//
//   metrics.rs    — per-epoch loss / EM / F1 rows in a CSV file
//
// Reference: Burn Book §5 (Checkpointing)

/// Model checkpoint saving and restoring
pub mod checkpoint;

/// Training metrics CSV logger
pub mod metrics;
