fn main() -> Result<(), Box<dyn std::error::Error>> {
    neuralcore::cli::main()
}
