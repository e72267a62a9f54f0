pub mod convolver;
pub mod curve;
pub mod delay_line;
pub mod effect;
pub mod gain;
pub mod param;
pub mod waveshaper;
