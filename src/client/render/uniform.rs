// Copyright © 2021 strogg developers
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Dynamic uniform buffer suballocation.
//!
//! Per-entity uniform blocks are carved out of one large buffer and addressed
//! with dynamic offsets, so a frame's worth of entities costs one bind group.

use std::marker::PhantomData;

use bytemuck::Pod;

const DYNAMIC_UNIFORM_BUFFER_SIZE: wgpu::BufferAddress = 1 << 20;

/// Required offset alignment for dynamic uniform binding.
pub const DYNAMIC_UNIFORM_BUFFER_ALIGNMENT: usize = 256;

/// A handle to a dynamic uniform buffer on the GPU.
///
/// Writes accumulate in a CPU shadow and are flushed once per frame.
pub struct DynamicUniformBuffer<T>
where
    T: Pod,
{
    _phantom: PhantomData<T>,
    inner: wgpu::Buffer,
    allocated: u64,
    update_buf: Vec<u8>,
}

impl<T> DynamicUniformBuffer<T>
where
    T: Pod,
{
    pub fn new(device: &wgpu::Device) -> DynamicUniformBuffer<T> {
        let inner = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("dynamic uniform buffer"),
            size: DYNAMIC_UNIFORM_BUFFER_SIZE,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        DynamicUniformBuffer {
            _phantom: PhantomData,
            inner,
            allocated: 0,
            update_buf: vec![0; DYNAMIC_UNIFORM_BUFFER_SIZE as usize],
        }
    }

    pub fn block_size() -> wgpu::BufferAddress {
        std::mem::size_of::<T>()
            .next_multiple_of(DYNAMIC_UNIFORM_BUFFER_ALIGNMENT) as wgpu::BufferAddress
    }

    /// Allocates a block with the given initial value.
    #[must_use]
    pub fn allocate(&mut self, val: T) -> DynamicUniformBufferBlock<T> {
        let size = Self::block_size();
        assert!(
            self.allocated + size <= DYNAMIC_UNIFORM_BUFFER_SIZE,
            "dynamic uniform buffer exhausted"
        );

        let block = DynamicUniformBufferBlock {
            _phantom: PhantomData,
            addr: self.allocated,
        };
        self.allocated += size;

        self.write_block(&block, val);
        block
    }

    pub fn write_block(&mut self, block: &DynamicUniformBufferBlock<T>, val: T) {
        let start = block.addr as usize;
        let end = start + std::mem::size_of::<T>();
        self.update_buf[start..end].copy_from_slice(bytemuck::bytes_of(&val));
    }

    /// Drops every allocation. Outstanding blocks become dangling and must
    /// not be reused; callers reset their block lists alongside this.
    pub fn clear(&mut self) {
        self.allocated = 0;
    }

    pub fn flush(&self, queue: &wgpu::Queue) {
        queue.write_buffer(&self.inner, 0, &self.update_buf[..self.allocated as usize]);
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.inner
    }

    pub fn binding_size(&self) -> Option<wgpu::BufferSize> {
        wgpu::BufferSize::new(std::mem::size_of::<T>() as u64)
    }
}

/// An address into a dynamic uniform buffer.
#[derive(Debug)]
pub struct DynamicUniformBufferBlock<T> {
    _phantom: PhantomData<T>,
    addr: wgpu::BufferAddress,
}

impl<T> DynamicUniformBufferBlock<T> {
    pub fn offset(&self) -> wgpu::DynamicOffset {
        self.addr as wgpu::DynamicOffset
    }
}
