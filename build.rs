fn main() {
    // ESP-IDF link arguments are only needed for the firmware image; host
    // test builds run with `--no-default-features`.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
