pub mod imagewty;
