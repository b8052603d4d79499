fn main() -> anyhow::Result<()> {
  modbus_slave_lib::run()
}
