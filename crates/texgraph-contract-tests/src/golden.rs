#![forbid(unsafe_code)]

#[cfg(test)]
mod tests {
    use texgraph_eval::{
        BackendKind, CpuStore, EvalMask, Evaluation, FilterMode, InputSampler, NativeBackend,
    };
    use texgraph_nodes::{find_node_type, node_desc, zeroed_params, ParamBlockMut};

    const SIZE: u32 = 64;
    const RADIUS: f32 = 0.8;
    const TRANSLATE_X: f32 = 0.25;

    /// Reference pipeline, written out independently of the engine: a hard
    /// circle of parameter radius `RADIUS` (actual radius `RADIUS/2` around
    /// the center), then a quarter-turn translation on U with repeat wrap and
    /// nearest sampling.
    fn reference_pixels() -> Vec<u8> {
        let n = SIZE as usize;
        let circle_at = |x: usize, y: usize| -> u8 {
            let u = (x as f32 + 0.5) / SIZE as f32;
            let v = (y as f32 + 0.5) / SIZE as f32;
            let d = ((u - 0.5).powi(2) + (v - 0.5).powi(2)).sqrt();
            if d <= RADIUS * 0.5 {
                255
            } else {
                0
            }
        };

        let mut out = vec![0u8; n * n * 4];
        for y in 0..n {
            for x in 0..n {
                let u = (x as f32 + 0.5) / SIZE as f32;
                let su = (u - TRANSLATE_X).rem_euclid(1.0);
                let sx = ((su * SIZE as f32) as usize).min(n - 1);
                let value = circle_at(sx, y);
                let px = (y * n + x) * 4;
                out[px] = value;
                out[px + 1] = value;
                out[px + 2] = value;
                out[px + 3] = 255;
            }
        }
        out
    }

    /// Golden contract: a Circle feeding a Transform at 64x64 reproduces the
    /// reference pipeline byte for byte on the CPU backend.
    #[test]
    fn circle_into_transform_matches_reference() {
        let mut eval = Evaluation::new();
        eval.register_backend(BackendKind::Native, Box::new(NativeBackend::new()));
        let mut store = CpuStore::new();

        let circle_ty = find_node_type("Circle").unwrap();
        let circle = eval.add_evaluation(circle_ty).unwrap();
        eval.set_evaluation_mask(circle, EvalMask::NATIVE).unwrap();
        let mut params = zeroed_params(circle_ty).unwrap();
        ParamBlockMut::new(node_desc(circle_ty).unwrap(), &mut params)
            .unwrap()
            .set_float(0, 0, RADIUS);
        eval.set_evaluation_parameters(circle, &params).unwrap();
        eval.set_evaluation_size(circle, SIZE, SIZE).unwrap();

        let transform_ty = find_node_type("Transform").unwrap();
        let transform = eval.add_evaluation(transform_ty).unwrap();
        eval.set_evaluation_mask(transform, EvalMask::NATIVE).unwrap();
        let mut params = zeroed_params(transform_ty).unwrap();
        {
            let mut block = ParamBlockMut::new(node_desc(transform_ty).unwrap(), &mut params).unwrap();
            block.set_float(0, 0, TRANSLATE_X);
            block.set_float(2, 0, 1.0);
        }
        eval.set_evaluation_parameters(transform, &params).unwrap();
        eval.set_evaluation_size(transform, SIZE, SIZE).unwrap();
        eval.set_evaluation_sampler(
            transform,
            0,
            InputSampler {
                filter_min: FilterMode::Nearest,
                filter_mag: FilterMode::Nearest,
                ..InputSampler::default()
            },
        )
        .unwrap();

        eval.add_evaluation_input(transform, 0, circle).unwrap();
        eval.set_evaluation_order(vec![circle, transform]);
        eval.evaluate_all(&mut store).unwrap();

        let img = eval.get_evaluation_image(transform, &store).unwrap();
        assert_eq!((img.width(), img.height()), (SIZE, SIZE));
        assert_eq!(img.bytes(), reference_pixels().as_slice());
    }
}
