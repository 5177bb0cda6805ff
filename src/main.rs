fn main() {
    std::process::exit(server_orchestrator_lib::run());
}
