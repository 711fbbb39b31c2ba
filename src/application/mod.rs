// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Orchestrates the other layers to accomplish one goal each
// (training, inference).
//
// Rules for this layer:
//   - No ML math or model code here
//   - No UI or printing here (that's Layer 1)
//   - Only workflow coordination and the hyper-parameter file
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

/// The JSON hyper-parameter file and its conversion into configs
pub mod hyperparams;

// The training workflow
pub mod train_use_case;

// The span-prediction workflow
pub mod infer_use_case;
