//! Protocol binding (de)serialization errors

use derive_more::{Display, Error};

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum BindingError {
	#[display("RelayState is {length} bytes long, the binding allows at most {max}")]
	RelayStateTooLong { length: usize, max: usize },

	#[display("Unable to serialize the protocol message: {message}")]
	Serialization { message: String },

	#[display("Unable to decode the protocol message: {message}")]
	Decode { message: String },
}

impl BindingError {
	pub fn serialization(message: impl ToString) -> Self {
		Self::Serialization {
			message: message.to_string(),
		}
	}

	pub fn decode(message: impl ToString) -> Self {
		Self::Decode {
			message: message.to_string(),
		}
	}
}
