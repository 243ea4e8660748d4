mod frame_reading;
mod ordering;
mod validation;
