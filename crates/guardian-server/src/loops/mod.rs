//! Background loops for continuous processing.

pub mod presence_loop;
pub mod tick_loop;
