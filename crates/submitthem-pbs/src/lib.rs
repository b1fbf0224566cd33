//! PBS integration for submitthem.
//!
//! Build `qsub` scripts, parse `qsub`/`qstat` output and cancel with `qdel`.

pub mod backend;
pub mod qstat;
pub mod qsub;
pub mod script;

pub use backend::{Pbs, detect};
pub use qstat::{parse_state, read_info};
pub use qsub::{parse_submit_output, pbs_form};
pub use script::build_script;
