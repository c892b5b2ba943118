use tesctl::{DeviceController, Selector, Target, TesError};

fn main() -> Result<(), TesError> {
    env_logger::init();

    let controller = DeviceController::connect_serial("/dev/ttyACM0", 115_200)?;

    controller.tes_enable(Selector::all())?;
    controller.tes_set_current(vec![1, 3, 5], 2.5)?;

    for (channel, reply) in (1..).zip(controller.tes_get_current(Selector::all())?.into_vec()) {
        println!("TES {channel}: {:?} mA", reply.get("current_mA"));
    }

    controller.lna_enable(1, Target::Gate)?;
    let gate = controller.lna_get_all(1, Target::Gate)?;
    println!("LNA 1 gate: {:?}", gate.into_one());

    controller.tes_disable(Selector::all())?;
    Ok(())
}
