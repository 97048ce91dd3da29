//! Shared fixtures for unit tests: descriptor builders and a demo schema.

use crate::registry::DescriptorRegistry;
use prost::Message;
use prost_reflect::{DescriptorPool, DynamicMessage};
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto, FileDescriptorSet, MessageOptions,
};

pub(crate) fn field(
    name: &str,
    number: i32,
    ty: Type,
    repeated: bool,
    type_name: Option<&str>,
) -> FieldDescriptorProto {
    let label = if repeated {
        Label::Repeated
    } else {
        Label::Optional
    };
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(label as i32),
        r#type: Some(ty as i32),
        type_name: type_name.map(str::to_string),
        ..Default::default()
    }
}

pub(crate) fn message(name: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.to_string()),
        field: fields,
        ..Default::default()
    }
}

pub(crate) fn map_entry(name: &str, key: Type, value: Type, value_type: Option<&str>) -> DescriptorProto {
    DescriptorProto {
        options: Some(MessageOptions {
            map_entry: Some(true),
            ..Default::default()
        }),
        ..message(
            name,
            vec![
                field("key", 1, key, false, None),
                field("value", 2, value, false, value_type),
            ],
        )
    }
}

pub(crate) fn enumeration(name: &str, values: &[(&str, i32)]) -> EnumDescriptorProto {
    EnumDescriptorProto {
        name: Some(name.to_string()),
        value: values
            .iter()
            .map(|(name, number)| EnumValueDescriptorProto {
                name: Some(name.to_string()),
                number: Some(*number),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

pub(crate) fn file(
    name: &str,
    package: &str,
    messages: Vec<DescriptorProto>,
    enums: Vec<EnumDescriptorProto>,
) -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(name.to_string()),
        package: (!package.is_empty()).then(|| package.to_string()),
        message_type: messages,
        enum_type: enums,
        syntax: Some("proto3".to_string()),
        ..Default::default()
    }
}

pub(crate) fn encode_set(files: Vec<FileDescriptorProto>) -> Vec<u8> {
    FileDescriptorSet { file: files }.encode_to_vec()
}

/// Demo schema:
///
/// ```text
/// package demo;
/// enum Status { UNKNOWN = 0; ACTIVE = 1; DISABLED = 2; }
/// message Point { int32 x = 1; int32 y = 2; }
/// message User {
///   int32 id = 1; string name = 2; Status status = 3; repeated int32 scores = 4;
///   Point location = 5; map<string, int64> counters = 6; repeated string tags = 7;
///   sint64 delta = 8; bytes avatar = 9; double ratio = 10; bool active = 11;
///   fixed32 crc = 12; repeated Point friends = 13; repeated Status history = 14;
///   map<int32, Point> places = 15;
/// }
/// message Ping { uint64 seq = 1; }
/// message Envelope { message Header { uint64 ts = 1; string source = 2; } Header header = 1; bytes payload = 2; }
/// message Numbers {
///   float f = 1; sfixed32 sf32 = 2; sfixed64 sf64 = 3; fixed64 f64 = 4; sint32 s32 = 5;
///   uint32 u32 = 6; uint64 u64 = 7; int64 i64 = 8; repeated float samples = 9;
/// }
/// // no package
/// message T { int32 id = 1; }
/// ```
pub(crate) fn demo_set() -> Vec<u8> {
    let mut user = message(
        "User",
        vec![
            field("id", 1, Type::Int32, false, None),
            field("name", 2, Type::String, false, None),
            field("status", 3, Type::Enum, false, Some(".demo.Status")),
            field("scores", 4, Type::Int32, true, None),
            field("location", 5, Type::Message, false, Some(".demo.Point")),
            field("counters", 6, Type::Message, true, Some(".demo.User.CountersEntry")),
            field("tags", 7, Type::String, true, None),
            field("delta", 8, Type::Sint64, false, None),
            field("avatar", 9, Type::Bytes, false, None),
            field("ratio", 10, Type::Double, false, None),
            field("active", 11, Type::Bool, false, None),
            field("crc", 12, Type::Fixed32, false, None),
            field("friends", 13, Type::Message, true, Some(".demo.Point")),
            field("history", 14, Type::Enum, true, Some(".demo.Status")),
            field("places", 15, Type::Message, true, Some(".demo.User.PlacesEntry")),
        ],
    );
    user.nested_type = vec![
        map_entry("CountersEntry", Type::String, Type::Int64, None),
        map_entry("PlacesEntry", Type::Int32, Type::Message, Some(".demo.Point")),
    ];

    let mut envelope = message(
        "Envelope",
        vec![
            field("header", 1, Type::Message, false, Some(".demo.Envelope.Header")),
            field("payload", 2, Type::Bytes, false, None),
        ],
    );
    envelope.nested_type = vec![message(
        "Header",
        vec![
            field("ts", 1, Type::Uint64, false, None),
            field("source", 2, Type::String, false, None),
        ],
    )];

    let demo = file(
        "demo.proto",
        "demo",
        vec![
            message(
                "Point",
                vec![
                    field("x", 1, Type::Int32, false, None),
                    field("y", 2, Type::Int32, false, None),
                ],
            ),
            user,
            message("Ping", vec![field("seq", 1, Type::Uint64, false, None)]),
            envelope,
            message(
                "Numbers",
                vec![
                    field("f", 1, Type::Float, false, None),
                    field("sf32", 2, Type::Sfixed32, false, None),
                    field("sf64", 3, Type::Sfixed64, false, None),
                    field("f64", 4, Type::Fixed64, false, None),
                    field("s32", 5, Type::Sint32, false, None),
                    field("u32", 6, Type::Uint32, false, None),
                    field("u64", 7, Type::Uint64, false, None),
                    field("i64", 8, Type::Int64, false, None),
                    field("samples", 9, Type::Float, true, None),
                ],
            ),
        ],
        vec![enumeration(
            "Status",
            &[("UNKNOWN", 0), ("ACTIVE", 1), ("DISABLED", 2)],
        )],
    );
    let t = file(
        "t.proto",
        "",
        vec![message("T", vec![field("id", 1, Type::Int32, false, None)])],
        vec![],
    );

    encode_set(vec![demo, t])
}

/// Registry with the demo schema loaded as "demo"
pub(crate) fn registry() -> DescriptorRegistry {
    let registry = DescriptorRegistry::new();
    registry
        .load("demo", &demo_set())
        .expect("demo schema loads");
    registry
}

/// Encode a message of the demo schema with prost-reflect
pub(crate) fn encode(type_name: &str, build: impl FnOnce(&mut DynamicMessage)) -> Vec<u8> {
    let pool = DescriptorPool::decode(demo_set().as_slice()).expect("demo schema links");
    let descriptor = pool
        .get_message_by_name(type_name)
        .expect("type exists in demo schema");
    let mut message = DynamicMessage::new(descriptor);
    build(&mut message);
    message.encode_to_vec()
}

/// Append a varint to `buf`
pub(crate) fn put_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Append a tag to `buf`
pub(crate) fn put_tag(buf: &mut Vec<u8>, number: u32, wire_type: u8) {
    put_varint(buf, ((number as u64) << 3) | wire_type as u64);
}

/// Append a length-delimited field to `buf`
pub(crate) fn put_len(buf: &mut Vec<u8>, number: u32, payload: &[u8]) {
    put_tag(buf, number, 2);
    put_varint(buf, payload.len() as u64);
    buf.extend_from_slice(payload);
}
