mod common;

mod priority;
