pub mod impute;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod queue;
pub mod storage;
pub mod tasks;
