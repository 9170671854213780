pub mod supervisor;

pub use supervisor::{check_python_setup, ProcessSupervisor, PythonSetupReport};
