mod descriptive;
mod value;

pub use self::descriptive::{CreatorSource, DescriptiveMetadata, MetadataType};
pub use self::value::{FieldValue, MetadataValue};
