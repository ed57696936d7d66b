use proxyvm_core::{FieldCollection, Host, MapType, MemoryHost};
use std::rc::Rc;

fn pairs(fields: &FieldCollection) -> Vec<(String, String)> {
    fields
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

#[test]
fn replaced_collection_reads_back_in_order() {
    let memory = Rc::new(MemoryHost::new());
    let host = Host::new(memory.clone());
    let fields = FieldCollection::from_pairs(vec![
        (":status", "200"),
        ("set-cookie", "a=1"),
        ("set-cookie", "b=2"),
        ("x-empty", ""),
        ("x-utf8", "grüße"),
    ]);

    host.set_fields(MapType::HttpResponseHeaders, &fields)
        .expect("wholesale replace");
    let read_back = host
        .get_fields(MapType::HttpResponseHeaders)
        .expect("read back");
    assert_eq!(pairs(&read_back), pairs(&fields));
    assert_eq!(memory.map(MapType::HttpResponseHeaders).len(), 5);
}

#[test]
fn per_key_mutation_reaches_the_host_without_reserializing() {
    let memory = Rc::new(MemoryHost::new());
    let host = Host::new(memory.clone());
    memory.set_map(
        MapType::HttpRequestHeaders,
        vec![(":path", "/"), ("x-debug", "1"), ("accept", "*/*")],
    );

    host.replace_field(MapType::HttpRequestHeaders, "accept", "application/json")
        .expect("replace");
    host.remove_field(MapType::HttpRequestHeaders, "x-debug")
        .expect("remove");
    host.add_field(MapType::HttpRequestHeaders, "x-trace", "on")
        .expect("add");

    assert_eq!(
        memory.map(MapType::HttpRequestHeaders),
        vec![
            (":path".to_string(), "/".to_string()),
            ("accept".to_string(), "application/json".to_string()),
            ("x-trace".to_string(), "on".to_string()),
        ]
    );
    assert_eq!(
        host.get_field(MapType::HttpRequestHeaders, "x-debug")
            .expect("lookup"),
        None
    );
}
