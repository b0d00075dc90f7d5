fn main() {
    studytime_lib::run()
}
