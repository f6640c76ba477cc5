//! Deterministic synthetic telemetry.
//!
//! Stands in for the live TH/VOC feed when none is reachable. Output is a
//! pure function of (site id, time range, config): every generation call
//! reseeds its own PRNG from the site id, so concurrent generations for
//! different sites never interfere.

pub mod emitter;
pub mod rng;
pub mod signal;

pub use emitter::{RowEmitter, Rows, TimeSteps};
pub use rng::{hash_site, XorShift32};
pub use signal::{daylight, Sample, SiteSignal};
