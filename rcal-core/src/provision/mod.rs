//! Provisioning system for rcal images.
//!
//! The image definition is an explicit ordered list of step descriptors,
//! statically validated and then executed by a small interpreter loop
//! that halts and reports on the first failure.

pub mod executor;
pub mod sequence;
pub mod step;

pub use executor::{execute_sequence, ProvisionState, StepRunner, SystemRunner};
pub use sequence::ProvisioningSequence;
pub use step::{ProvisioningStep, StepAction};
