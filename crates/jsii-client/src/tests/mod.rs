use super::*;

use std::sync::Arc;

use serde_json::{json, Value};

mod support;
use support::*;

mod engine_protocol;
mod marshal_values;
mod registry_identity;
