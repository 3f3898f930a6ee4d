fn main() -> anyhow::Result<()> {
    room_occupancy::cli::run()
}
