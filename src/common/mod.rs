/* Common */

pub mod log;
