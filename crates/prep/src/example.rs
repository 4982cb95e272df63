//! The subset of `tf.train.Example` this crate writes.
//!
//! Field numbers match `tensorflow/core/example/{example,feature}.proto`, so
//! the bytes are readable by any TensorFlow input pipeline.

use std::collections::BTreeMap;

use prost::Message;

#[derive(Clone, PartialEq, Message)]
pub struct Int64List {
    #[prost(int64, repeated, tag = "1")]
    pub value: Vec<i64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Feature {
    #[prost(oneof = "feature::Kind", tags = "3")]
    pub kind: Option<feature::Kind>,
}

pub mod feature {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "3")]
        Int64List(super::Int64List),
    }
}

impl Feature {
    pub fn int64s(value: Vec<i64>) -> Self {
        Self {
            kind: Some(feature::Kind::Int64List(Int64List { value })),
        }
    }

    pub fn as_int64s(&self) -> Option<&[i64]> {
        match &self.kind {
            Some(feature::Kind::Int64List(list)) => Some(&list.value),
            None => None,
        }
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct Features {
    #[prost(btree_map = "string, message", tag = "1")]
    pub feature: BTreeMap<String, Feature>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Example {
    #[prost(message, optional, tag = "1")]
    pub features: Option<Features>,
}

/// Feature key holding the token ids.
pub const FEATURE_KEY: &str = "feature";
/// Feature key holding the single label id.
pub const LABEL_KEY: &str = "label";

/// One training pair: `feature` = token ids, `label` = `[label]`.
pub fn training_example(ids: Vec<i64>, label: i64) -> Example {
    let mut feature = BTreeMap::new();
    feature.insert(FEATURE_KEY.to_owned(), Feature::int64s(ids));
    feature.insert(LABEL_KEY.to_owned(), Feature::int64s(vec![label]));
    Example {
        features: Some(Features { feature }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_encodes_as_tensorflow_expects() {
        // Features{ "label": Feature{ int64_list{ value: [2] } } }
        let example = Example {
            features: Some(Features {
                feature: BTreeMap::from([(LABEL_KEY.to_owned(), Feature::int64s(vec![2]))]),
            }),
        };
        let expected: &[u8] = &[
            0x0a, 0x10, // features
            0x0a, 0x0e, // map entry
            0x0a, 0x05, b'l', b'a', b'b', b'e', b'l', // key
            0x12, 0x05, // value: Feature
            0x1a, 0x03, // int64_list
            0x0a, 0x01, 0x02, // packed value [2]
        ];
        assert_eq!(example.encode_to_vec(), expected);
    }

    #[test]
    fn training_example_decodes_back() {
        let bytes = training_example(vec![101, 7, 102, 0], 1).encode_to_vec();
        let decoded = Example::decode(bytes.as_slice()).unwrap();
        let features = decoded.features.unwrap().feature;

        assert_eq!(features[FEATURE_KEY].as_int64s(), Some(&[101, 7, 102, 0][..]));
        assert_eq!(features[LABEL_KEY].as_int64s(), Some(&[1][..]));
    }
}
