mod console;
mod support;
