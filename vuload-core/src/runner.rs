mod iteration;
mod scheduler;
mod vu;

pub use iteration::{IterationContext, IterationFault, IterationOutcome, IterationRunner, TestFn};
pub(crate) use scheduler::{Scheduler, SchedulerEvent, SchedulerSettings};
