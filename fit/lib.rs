#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
pub mod basis;
pub mod data;
pub mod design;
pub mod family;
pub mod gam;
pub mod glm;
pub mod ppm;
pub mod workflow;

#[path = "../correct/mod.rs"]
pub mod correct;

#[path = "../report/mod.rs"]
pub mod report;
