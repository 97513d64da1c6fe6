pub mod etags;
pub mod flight;
pub mod generate;
pub mod janitor;
