fn main() -> std::process::ExitCode {
    paperless_scan_lib::run()
}
