pub async fn list() -> Vec<String> {
    vec!["ada".to_string(), "grace".to_string()]
}

seamless_rpc::procedure!(list);
