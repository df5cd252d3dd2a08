pub mod error;
pub mod settings;

// data module
pub mod data {
    pub mod key;
    pub mod store;
    pub mod index;
    pub mod targets;
    pub mod output;
    pub mod validator;
}

// run module
pub mod run {
    pub mod monitor;
    pub mod runner;
}
