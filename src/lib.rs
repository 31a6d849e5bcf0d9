pub mod data_table;
pub mod engine;
pub mod history;
pub mod instructions;
pub mod lab_objects;
pub mod optics;
pub mod render_graph;
pub mod shell;
pub mod view;
