pub mod imaging;
pub mod producer;
pub mod queue;
pub mod status;
pub mod storage;
pub mod worker;
