/*!
Module with basic types used in heapview.

This module contains the process word abstraction all analysis structures
are parameterized on.
*/

pub mod offset;
pub use offset::Offset;
