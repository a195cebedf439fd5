fn main() {
    spotlight_assistant_lib::run()
}
