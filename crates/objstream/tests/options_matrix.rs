use std::sync::Arc;

use objstream::{
    DecodeError, DecoderOptions, DescSpec, LocalClass, ObjectDecoder, StreamError, StreamWriter,
    TypeCode, TypeRegistry, Value, DEFAULT_MAX_DEPTH,
};

fn node_desc() -> DescSpec {
    DescSpec::serializable("com.acme.Node")
        .field("value", TypeCode::Int)
        .object_field("next", "Lcom/acme/Node;")
}

fn registry() -> Arc<TypeRegistry> {
    Arc::new(
        TypeRegistry::new()
            .with(
                LocalClass::serializable("com.acme.Node")
                    .field("value", TypeCode::Int)
                    .object_field("next", "Lcom/acme/Node;"),
            )
            .with(LocalClass::serializable("com.acme.evil.Gadget")),
    )
}

fn write_list(w: &mut StreamWriter, len: i32) {
    let desc = node_desc();
    for i in 0..len {
        w.begin_object(&desc);
        w.write_i32(i);
    }
    w.null();
    for _ in 0..len {
        w.end_object();
    }
}

fn decoder(bytes: &[u8], options: DecoderOptions) -> ObjectDecoder<'_> {
    ObjectDecoder::with_options(bytes, registry(), options).unwrap()
}

fn rejected(result: objstream::Result<Value>) -> bool {
    matches!(result, Err(DecodeError::Stream(StreamError::FilterRejected(_))))
}

#[test]
fn depth_limit_matrix() {
    let mut w = StreamWriter::new();
    write_list(&mut w, 2);
    let shallow = w.finish();
    let mut d = decoder(&shallow, DecoderOptions::new().with_max_depth(4));
    let head = d.read_object().unwrap();
    let next = d.heap().object(head).and_then(|o| o.get("next")).unwrap();
    assert_eq!(
        d.heap().object(next).and_then(|o| o.get("value")),
        Some(Value::Int(1))
    );

    let mut w = StreamWriter::new();
    write_list(&mut w, 10);
    let deep = w.finish();
    let mut d = decoder(&deep, DecoderOptions::new().with_max_depth(4));
    assert!(matches!(
        d.read_object(),
        Err(DecodeError::Stream(StreamError::DepthLimitExceeded(4)))
    ));
    assert!(d.handles().is_empty());

    let mut d = decoder(&deep, DecoderOptions::default());
    assert!(d.read_object().is_ok());
}

/// Runs `f` on a thread with a 2 MiB stack.
fn on_small_stack<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
    std::thread::Builder::new()
        .stack_size(2 << 20)
        .spawn(f)
        .unwrap()
        .join()
        .unwrap()
}

fn list_len(d: &ObjectDecoder<'_>, head: Value) -> usize {
    let mut len = 0;
    let mut node = head;
    while let Some(obj) = d.heap().object(node) {
        len += 1;
        node = obj.get("next").unwrap();
    }
    len
}

#[test]
fn default_depth_limit_matrix() {
    on_small_stack(|| {
        // n nodes nest n + 1 levels: the trailing null is a record too.
        let mut w = StreamWriter::new();
        write_list(&mut w, DEFAULT_MAX_DEPTH as i32 - 1);
        let at_limit = w.finish();
        let mut d = decoder(&at_limit, DecoderOptions::default());
        let head = d.read_object().unwrap();
        assert_eq!(list_len(&d, head), DEFAULT_MAX_DEPTH - 1);

        let mut w = StreamWriter::new();
        write_list(&mut w, DEFAULT_MAX_DEPTH as i32);
        let past_limit = w.finish();
        let mut d = decoder(&past_limit, DecoderOptions::default());
        assert!(matches!(
            d.read_object(),
            Err(DecodeError::Stream(StreamError::DepthLimitExceeded(DEFAULT_MAX_DEPTH)))
        ));
        assert!(d.handles().is_empty());

        let mut w = StreamWriter::new();
        write_list(&mut w, 10_000);
        let hostile = w.finish();
        let mut d = decoder(&hostile, DecoderOptions::default());
        assert!(matches!(
            d.read_object(),
            Err(DecodeError::Stream(StreamError::DepthLimitExceeded(_)))
        ));
    });
}

#[test]
fn array_length_limit_matrix() {
    let mut w = StreamWriter::new();
    w.int_array(&[1, 2, 3]);
    w.int_array(&[0; 100]);
    let bytes = w.finish();

    let mut d = decoder(&bytes, DecoderOptions::new().with_max_array_length(10));
    let small = d.read_object().unwrap();
    assert_eq!(d.heap().array(small).map(|a| a.data.len()), Some(3));
    assert!(rejected(d.read_object()));
}

#[test]
fn reference_limit_matrix() {
    let mut w = StreamWriter::new();
    w.string("one");
    w.string("two");
    w.string("three");
    let bytes = w.finish();

    let mut d = decoder(&bytes, DecoderOptions::new().with_max_references(2));
    assert!(d.read_object().is_ok());
    assert!(d.read_object().is_ok());
    assert!(rejected(d.read_object()));

    let mut w = StreamWriter::new();
    let first = w.string("one");
    w.back_ref(first);
    w.back_ref(first);
    let bytes = w.finish();
    let mut d = decoder(&bytes, DecoderOptions::new().with_max_references(1));
    let a = d.read_object().unwrap();
    assert_eq!(d.read_object().unwrap(), a);
    assert_eq!(d.read_object().unwrap(), a);
}

#[test]
fn stream_bytes_limit_matrix() {
    let mut w = StreamWriter::new();
    w.string("twenty characters...");
    w.string("after the limit");
    let bytes = w.finish();

    let mut d = decoder(&bytes, DecoderOptions::new().with_max_stream_bytes(16));
    assert!(d.read_object().is_ok());
    assert!(rejected(d.read_object()));
}

#[test]
fn type_filter_matrix() {
    let mut w = StreamWriter::new();
    write_list(&mut w, 1);
    w.begin_object(&DescSpec::serializable("com.acme.evil.Gadget"));
    w.end_object();
    let bytes = w.finish();

    let opts = DecoderOptions::new().allow("com.acme.**").deny("com.acme.evil.*");
    let mut d = decoder(&bytes, opts);
    assert!(d.read_object().is_ok());
    assert!(rejected(d.read_object()));

    let mut d = decoder(&bytes, DecoderOptions::new().allow("org.other.*"));
    assert!(rejected(d.read_object()));

    let mut d = decoder(&bytes, DecoderOptions::new().allow("com.*.Node"));
    assert!(d.read_object().is_ok());
    assert!(rejected(d.read_object()));
}

#[test]
fn array_component_filter_matrix() {
    let mut w = StreamWriter::new();
    w.begin_array(&DescSpec::array("[Lcom.acme.evil.Gadget;"), 0);
    w.end_array();
    w.int_array(&[1]);
    let bytes = w.finish();

    let mut d = decoder(&bytes, DecoderOptions::new().deny("com.acme.evil.Gadget"));
    assert!(rejected(d.read_object()));

    let mut w = StreamWriter::new();
    w.int_array(&[1]);
    let bytes = w.finish();
    let mut d = decoder(&bytes, DecoderOptions::new().allow("com.acme.*"));
    assert!(d.read_object().is_ok());
}

#[test]
fn options_from_toml_matrix() {
    let opts: DecoderOptions = toml::from_str(
        r#"
            max_depth = 16
            max_array_length = 4096
            allow_types = ["com.acme.**"]
            deny_types = ["com.acme.evil.*"]
        "#,
    )
    .unwrap();
    assert_eq!(opts.max_depth, 16);
    assert_eq!(opts.max_array_length, Some(4096));
    assert_eq!(opts.max_references, None);
    assert_eq!(opts.allow_types, vec!["com.acme.**".to_owned()]);

    let empty: DecoderOptions = toml::from_str("").unwrap();
    assert_eq!(empty, DecoderOptions::default());

    let text = toml::to_string(&opts).unwrap();
    let back: DecoderOptions = toml::from_str(&text).unwrap();
    assert_eq!(back, opts);
}

#[test]
fn options_from_json_matrix() {
    let opts: DecoderOptions =
        serde_json::from_str(r#"{"max_references": 3, "deny_types": ["*"]}"#).unwrap();
    assert_eq!(opts.max_references, Some(3));
    assert!(opts.check_type("anything").is_err());
    assert!(opts.check_type("[J").is_ok());
}
