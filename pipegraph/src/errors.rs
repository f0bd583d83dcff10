#[derive(thiserror::Error, Debug)]
pub enum ConnectError {
    #[error(
        "type mismatch: {from_module}.{from_port} carries {from_type} but \
         {to_module}.{to_port} expects {to_type}"
    )]
    TypeMismatch {
        from_module: String,
        from_port: String,
        from_type: &'static str,
        to_module: String,
        to_port: String,
        to_type: &'static str,
    },
    #[error("cannot connect {module}.{from_port} to {module}.{to_port}: self loop")]
    SelfLoop {
        module: String,
        from_port: String,
        to_port: String,
    },
    #[error("wrong direction: expected output -> input, got {got}")]
    WrongDirection { got: String },
}

#[derive(thiserror::Error, Debug)]
pub enum StartupError {
    #[error("wiring failed: {0}")]
    Connect(#[from] ConnectError),
    #[error("required parameter {param} of module {module} is not set")]
    RequiredParamUnset { module: String, param: String },
    #[error("input {module}.{input} has no handler and no relay")]
    MissingHandler { module: String, input: String },
    #[error("module {module} failed to start: {source}")]
    ModuleStart {
        module: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
