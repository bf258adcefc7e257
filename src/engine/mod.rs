pub mod coordinator;
pub mod lifecycle;
pub mod ranking;
pub mod slots;
pub mod travel;
