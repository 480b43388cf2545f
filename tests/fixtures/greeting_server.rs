use seamless_rpc::RpcError;

pub async fn greet(name: String) -> String {
    format!("Hello, {name}!")
}

pub async fn farewell(name: String) -> Result<String, RpcError> {
    if name.is_empty() {
        return Err(RpcError::validation("name is required"));
    }
    Ok(format!("Goodbye, {name}!"))
}

seamless_rpc::procedure!(greet, farewell);
