//! TensorBoard protobuf messages stored in event files.
//!
//! Only the subset of `event.proto`, `summary.proto` and `tensor.proto`
//! needed to write and read scalar summaries.

/// Protocol version written as the first event of every file.
pub const FILE_VERSION: &str = "brain.Event:2";

/// Plugin that renders scalar tensors.
pub const SCALARS_PLUGIN: &str = "scalars";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Event {
    /// Seconds since the Unix epoch.
    #[prost(double, tag = "1")]
    pub wall_time: f64,
    #[prost(int64, tag = "2")]
    pub step: i64,
    #[prost(oneof = "event::What", tags = "3, 5")]
    pub what: ::core::option::Option<event::What>,
}

pub mod event {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum What {
        #[prost(string, tag = "3")]
        FileVersion(::prost::alloc::string::String),
        #[prost(message, tag = "5")]
        Summary(super::Summary),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Summary {
    #[prost(message, repeated, tag = "1")]
    pub value: ::prost::alloc::vec::Vec<summary::Value>,
}

pub mod summary {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Value {
        #[prost(string, tag = "1")]
        pub tag: ::prost::alloc::string::String,
        #[prost(message, optional, tag = "9")]
        pub metadata: ::core::option::Option<super::SummaryMetadata>,
        #[prost(oneof = "value::Value", tags = "2, 8")]
        pub value: ::core::option::Option<value::Value>,
    }

    pub mod value {
        #[derive(Clone, PartialEq, ::prost::Oneof)]
        pub enum Value {
            #[prost(float, tag = "2")]
            SimpleValue(f32),
            #[prost(message, tag = "8")]
            Tensor(super::super::TensorProto),
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SummaryMetadata {
    #[prost(message, optional, tag = "1")]
    pub plugin_data: ::core::option::Option<summary_metadata::PluginData>,
}

pub mod summary_metadata {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct PluginData {
        #[prost(string, tag = "1")]
        pub plugin_name: ::prost::alloc::string::String,
        #[prost(bytes = "vec", tag = "2")]
        pub content: ::prost::alloc::vec::Vec<u8>,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TensorProto {
    #[prost(enumeration = "DataType", tag = "1")]
    pub dtype: i32,
    #[prost(message, optional, tag = "2")]
    pub tensor_shape: ::core::option::Option<TensorShapeProto>,
    #[prost(float, repeated, tag = "5")]
    pub float_val: ::prost::alloc::vec::Vec<f32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TensorShapeProto {
    #[prost(message, repeated, tag = "2")]
    pub dim: ::prost::alloc::vec::Vec<tensor_shape_proto::Dim>,
    #[prost(bool, tag = "3")]
    pub unknown_rank: bool,
}

pub mod tensor_shape_proto {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Dim {
        #[prost(int64, tag = "1")]
        pub size: i64,
        #[prost(string, tag = "2")]
        pub name: ::prost::alloc::string::String,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum DataType {
    DtInvalid = 0,
    DtFloat = 1,
}

impl summary::Value {
    /// A classic `simple_value` scalar.
    #[must_use]
    pub fn simple(tag: &str, value: f32) -> Self {
        Self {
            tag: tag.to_string(),
            metadata: None,
            value: Some(summary::value::Value::SimpleValue(value)),
        }
    }

    /// A rank-0 float tensor tagged for the scalars plugin.
    #[must_use]
    pub fn scalar_tensor(tag: &str, value: f32) -> Self {
        Self {
            tag: tag.to_string(),
            metadata: Some(SummaryMetadata {
                plugin_data: Some(summary_metadata::PluginData {
                    plugin_name: SCALARS_PLUGIN.to_string(),
                    content: Vec::new(),
                }),
            }),
            value: Some(summary::value::Value::Tensor(TensorProto {
                dtype: DataType::DtFloat as i32,
                tensor_shape: Some(TensorShapeProto::default()),
                float_val: vec![value],
            })),
        }
    }

    /// The scalar carried by this value, whichever style it was written in.
    #[must_use]
    pub fn scalar(&self) -> Option<f32> {
        match &self.value {
            Some(summary::value::Value::SimpleValue(v)) => Some(*v),
            Some(summary::value::Value::Tensor(t)) => t.float_val.first().copied(),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_simple_value_round_trip() {
        let event = Event {
            wall_time: 1.5,
            step: 7,
            what: Some(event::What::Summary(Summary {
                value: vec![summary::Value::simple("Loss/surrogate", 0.25)],
            })),
        };
        let decoded = Event::decode(event.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_scalar_tensor_carries_plugin_metadata() {
        let value = summary::Value::scalar_tensor("Train/mean_reward", 3.0);
        let plugin = value.metadata.as_ref().and_then(|m| m.plugin_data.as_ref()).unwrap();
        assert_eq!(plugin.plugin_name, SCALARS_PLUGIN);
        assert_eq!(value.scalar(), Some(3.0));
    }

    #[test]
    fn test_file_version_encoding_is_stable() {
        let event = Event {
            wall_time: 0.0,
            step: 0,
            what: Some(event::What::FileVersion(FILE_VERSION.to_string())),
        };
        // tag 3, wire type 2, length 13, then the version string
        let bytes = event.encode_to_vec();
        assert_eq!(bytes[0], 0x1a);
        assert_eq!(bytes[1], 13);
        assert_eq!(&bytes[2..], FILE_VERSION.as_bytes());
    }
}
