//! Offline evaluation demo: build a two-stage graph (Circle -> Transform),
//! evaluate it entirely on the CPU backend, and write the result as a PNG.
//!
//! Run with: `cargo run -p native_offline -- out.png`

use texgraph_eval::{BackendKind, CpuStore, EvalMask, Evaluation, NativeBackend};
use texgraph_image::codec;
use texgraph_nodes::{find_node_type, node_desc, zeroed_params, ParamBlockMut};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let out_path = std::env::args().nth(1).unwrap_or_else(|| "out.png".into());

    let mut eval = Evaluation::new();
    eval.register_backend(BackendKind::Native, Box::new(NativeBackend::new()));
    let mut store = CpuStore::new();

    let circle_ty = find_node_type("Circle").ok_or("missing Circle node type")?;
    let circle = eval.add_evaluation(circle_ty)?;
    eval.set_evaluation_mask(circle, EvalMask::NATIVE)?;
    let mut params = zeroed_params(circle_ty)?;
    ParamBlockMut::new(node_desc(circle_ty)?, &mut params)?.set_float(0, 0, 0.7);
    eval.set_evaluation_parameters(circle, &params)?;
    eval.set_evaluation_size(circle, 256, 256)?;

    let transform_ty = find_node_type("Transform").ok_or("missing Transform node type")?;
    let transform = eval.add_evaluation(transform_ty)?;
    eval.set_evaluation_mask(transform, EvalMask::NATIVE)?;
    let mut params = zeroed_params(transform_ty)?;
    {
        let mut block = ParamBlockMut::new(node_desc(transform_ty)?, &mut params)?;
        block.set_float(0, 0, 0.25); // Translate.x
        block.set_angle_degrees(1, 0, 30.0);
        block.set_float(2, 0, 1.5); // Scale
    }
    eval.set_evaluation_parameters(transform, &params)?;
    eval.set_evaluation_size(transform, 256, 256)?;

    eval.add_evaluation_input(transform, 0, circle)?;
    eval.set_evaluation_order(vec![circle, transform]);
    eval.evaluate_all(&mut store)?;

    let img = eval.get_evaluation_image(transform, &store)?;
    codec::write_image(&out_path, &img)?;
    println!("wrote {out_path} ({}x{})", img.width(), img.height());

    Ok(())
}
