pub mod counters;
pub mod packet;
pub mod result;
pub mod specialist;
pub mod state;
