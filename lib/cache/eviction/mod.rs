/// Second-chance clock sweep.
pub mod clock;
