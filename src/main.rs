fn main() -> color_eyre::Result<()> {
    booking_data::run()
}
