use rmpv::Value;

/// Encode a host-binary marker the way the offline tool writes it.
pub fn marker_bytes(kernel_name: &str, paths: &[&str]) -> Vec<u8> {
    let value = Value::Map(vec![
        (Value::from("kernel_name"), Value::from(kernel_name)),
        (
            Value::from("kpack_search_paths"),
            Value::Array(paths.iter().map(|p| Value::from(*p)).collect()),
        ),
    ]);
    let mut bytes = Vec::new();
    rmpv::encode::write_value(&mut bytes, &value).expect("encode marker");
    bytes
}
