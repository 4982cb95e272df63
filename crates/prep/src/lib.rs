//! `prep` crate — turns cleaned text records into a TFRecord training set.
//!
//! Records are tokenized to fixed-length id sequences, paired with integer
//! labels, serialized as `tf.train.Example` protobufs and framed as
//! TFRecords.

pub mod component;
pub mod error;
pub mod example;
pub mod tfrecord;
pub mod tokenizer;

pub use component::{prepare_data, PrepSummary, PrepareDataConfig, PrepareDataNode, PREPARE_DATA};
pub use error::PrepError;
pub use tokenizer::{HfTokenizer, TextTokenizer};
