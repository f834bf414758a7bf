pub mod string_interning;
