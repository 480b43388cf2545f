pub async fn internal() -> u32 {
    42
}

seamless_rpc::procedure!(internal);
