#![forbid(unsafe_code)]

//! Cross-crate contract tests for the texgraph engine surface.
//!
//! These pin down the observable behaviors hosts rely on: parameter-block
//! layout, dense-index renumbering on delete, call-string determinism, the
//! angle editing boundary, pointer-driven parameter edits, error-indicator
//! containment, and resource-lifecycle accounting.

#[cfg(test)]
mod tests {
    use texgraph_nodes::{
        call_string, find_node_type, node_desc, zeroed_params, ParamBlock, ParamBlockMut,
        NODE_TYPES,
    };

    /// Layout contract: a node's parameter block is exactly the sum of its
    /// field sizes, in declaration order.
    #[test]
    fn parameter_blocks_are_field_size_sums() {
        for (ty, desc) in NODE_TYPES.iter().enumerate() {
            let by_sum: usize = desc.params.iter().map(|p| p.kind.byte_len()).sum();
            assert_eq!(desc.param_block_size(), by_sum, "{}", desc.name);
            assert_eq!(zeroed_params(ty).unwrap().len(), by_sum, "{}", desc.name);

            let mut off = 0;
            for (i, p) in desc.params.iter().enumerate() {
                assert_eq!(desc.field_offset(i), off, "{} field {}", desc.name, i);
                off += p.kind.byte_len();
            }
        }
    }

    /// Determinism contract: the call string is a pure function of
    /// `(node type, parameter bytes)` and is sensitive to every byte.
    #[test]
    fn call_strings_are_deterministic() {
        for (ty, desc) in NODE_TYPES.iter().enumerate() {
            let params = zeroed_params(ty).unwrap();
            let a = call_string(ty, &params).unwrap();
            let b = call_string(ty, &params).unwrap();
            assert_eq!(a, b, "{}", desc.name);
            assert!(a.starts_with(&format!("{}(vUV", desc.name)));

            // Flipping the sign bit of the first field changes the rendered
            // value (floats print -0.000000, integers go negative), so the
            // string must change with it.
            if !params.is_empty() {
                let mut mutated = params.clone();
                mutated[3] ^= 0x80;
                assert_ne!(call_string(ty, &mutated).unwrap(), a, "{}", desc.name);
            }
        }
    }

    /// Angle contract: hosts edit degrees, storage is radians, and the
    /// round-trip is stable to display precision.
    #[test]
    fn angle_editing_round_trips_through_degrees() {
        let ty = find_node_type("Transform").unwrap();
        let desc = node_desc(ty).unwrap();
        for degrees in [-720.0f32, -90.0, 0.0, 45.0, 90.0, 180.0, 359.5] {
            let mut bytes = zeroed_params(ty).unwrap();
            ParamBlockMut::new(desc, &mut bytes)
                .unwrap()
                .set_angle_degrees(1, 0, degrees);
            let block = ParamBlock::new(desc, &bytes).unwrap();
            assert!((block.float(1, 0) - degrees.to_radians()).abs() < 1e-4);
            assert!((block.angle_degrees(1, 0) - degrees).abs() < 1e-3);
        }
    }

    /// Pointer contract: a normalized drag maps linearly onto each declared
    /// range and hits both endpoints exactly, including reversed ranges.
    #[test]
    fn pointer_edits_respect_declared_ranges() {
        use texgraph_nodes::apply_pointer;

        let ty = find_node_type("Circle").unwrap();
        let desc = node_desc(ty).unwrap();
        let mut bytes = zeroed_params(ty).unwrap();
        for (rx, expected) in [(0.0f32, 0.0f32), (1.0, 1.0), (0.5, 0.5)] {
            apply_pointer(ty, &mut bytes, rx, 0.0).unwrap();
            assert_eq!(ParamBlock::new(desc, &bytes).unwrap().float(0, 0), expected);
        }

        // Transform's Translate declares reversed ranges (1 -> 0) on both
        // axes: pointer at the origin lands on the range start, not zero.
        let ty = find_node_type("Transform").unwrap();
        let desc = node_desc(ty).unwrap();
        let mut bytes = zeroed_params(ty).unwrap();
        apply_pointer(ty, &mut bytes, 0.0, 0.0).unwrap();
        let block = ParamBlock::new(desc, &bytes).unwrap();
        assert_eq!(block.float(0, 0), 1.0);
        assert_eq!(block.float(0, 1), 1.0);
        apply_pointer(ty, &mut bytes, 1.0, 1.0).unwrap();
        let block = ParamBlock::new(desc, &bytes).unwrap();
        assert_eq!(block.float(0, 0), 0.0);
        assert_eq!(block.float(0, 1), 0.0);
    }
}

mod graph_contracts;
mod golden;
