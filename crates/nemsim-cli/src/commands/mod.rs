pub mod batch;
pub mod plan;
pub mod report;
pub mod run;
pub mod util;
